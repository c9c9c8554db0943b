//! ---
//! rl_section: "02-remote-api"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Protobuf definitions and generated gRPC bindings."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
fn main() {
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("failed to locate protoc");
    std::env::set_var("PROTOC", protoc);

    println!("cargo:rerun-if-changed=proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(
            &[
                "proto/racelog/common/v1/common.proto",
                "proto/racelog/track/v1/track.proto",
                "proto/racelog/event/v1/event.proto",
                "proto/racelog/provider/v1/provider.proto",
                "proto/racelog/racestate/v1/racestate.proto",
            ],
            &["proto"],
        )
        .expect("failed to compile gRPC definitions");
}
