fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/credit.proto");
    println!("cargo:rerun-if-changed=proto");

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(false)
        .compile(&["proto/credit.proto"], &["proto"])?;
    Ok(())
}
