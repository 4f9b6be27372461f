use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let proto_root = Path::new("proto");
    let proto_path = proto_root.join("digger/events.proto");

    println!("cargo:rerun-if-changed={}", proto_path.display());

    let mut config = prost_build::Config::new();

    // Derive serde on every generated type so decoded messages can be
    // rendered to JSON through serde_json.
    config.type_attribute(".", "#[derive(::serde::Serialize, ::serde::Deserialize)]");
    config.type_attribute(".", "#[serde(default)]");

    config.compile_protos(&[proto_path], &[proto_root])?;

    Ok(())
}
