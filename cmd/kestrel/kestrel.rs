use clap::Parser;
use kestrel::cli::CLI;
use kestrel::initializers::init_tracing;

fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    init_tracing(&opts);
    command.run(&opts)
}
