fn main() {
    println!("cargo:rerun-if-changed=resources/windows/app.rc");
    println!("cargo:rerun-if-changed=resources/windows/app.manifest");
    println!("cargo:rerun-if-changed=resources/windows/app.ico");

    // Only embed the resource script when building for Windows
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        let _ = embed_resource::compile("resources/windows/app.rc", embed_resource::NONE);
    }
}
