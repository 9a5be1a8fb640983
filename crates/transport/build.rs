fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()?;
        // SAFETY: build scripts run single-threaded; tonic-build reads PROTOC from the env.
        unsafe {
            std::env::set_var("PROTOC", protoc);
        }
    }
    println!("cargo:rerun-if-changed=proto/nimbus.proto");
    tonic_build::configure()
        .build_client(false)
        .compile_protos(&["proto/nimbus.proto"], &["proto"])?;
    Ok(())
}
