mod cli;
mod config;

use cli::Registry;

fn main() {
    let mut registry = Registry::new();
    cli::manager::register(&mut registry);
    cli::rproxy::register(&mut registry);

    cli::execute(&registry);
}
