pub mod helpers;

mod builder_agreement;
mod function_cache;
mod stack_depth;
mod strict_reparse;
