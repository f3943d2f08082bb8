//! Version command implementation.

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

pub fn run() {
    println!("{NAME} {VERSION}");
    println!();
    println!("A Dynamo-style replicated key-value store.");
    println!();
    println!("Build info:");
    println!("  Rust version: {}", rustc_version());
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
}

fn rustc_version() -> &'static str {
    "1.88+"
}
