use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Host builds run the unit tests, which need no linker scripts
    if env::var("TARGET").as_deref() != Ok("thumbv8m.main-none-eabihf") {
        return;
    }

    // stm32 specific
    println!("cargo:rustc-link-arg=-Tlink.x");

    // add linker script for embedded-test!!
    println!("cargo::rustc-link-arg-tests=-Tembedded-test.x");

    // The on-target tests log through defmt-rtt
    println!("cargo::rustc-link-arg-tests=-Tdefmt.x");

    // Check if the `defmt` feature is enabled, and if so link its linker script
    if env::var("CARGO_FEATURE_DEFMT").is_ok() {
        println!("cargo:rustc-link-arg=-Tdefmt.x");
    }
}
