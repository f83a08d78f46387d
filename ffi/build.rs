//! Generates `include/cloudxfer.h` from the `extern "C"` surface.

use std::path::PathBuf;

fn main() {
    let crate_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    println!("cargo:rerun-if-changed=src");

    let generated = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("CLOUDXFER_H")
        .with_cpp_compat(true)
        .generate();

    match generated {
        Ok(bindings) => {
            let include = crate_dir.join("include");
            if let Err(err) = std::fs::create_dir_all(&include) {
                println!("cargo:warning=cannot create {}: {err}", include.display());
                return;
            }
            bindings.write_to_file(include.join("cloudxfer.h"));
        }
        Err(err) => println!("cargo:warning=cloudxfer.h not generated: {err}"),
    }
}
