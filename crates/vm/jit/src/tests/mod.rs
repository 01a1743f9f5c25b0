pub mod helpers;

mod call_linking;
mod jettison;
mod optimizing;
mod tiering;
mod unlinked;
