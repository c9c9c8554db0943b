//! ---
//! rl_section: "02-remote-api"
//! rl_subsection: "module"
//! rl_type: "source"
//! rl_scope: "code"
//! rl_description: "Protobuf definitions and generated gRPC bindings."
//! rl_version: "v0.1.0"
//! rl_owner: "tbd"
//! ---
//! Generated protobuf modules for the racelog service, re-exported under a
//! stable path so the rest of the workspace never touches codegen output
//! locations directly.

#[allow(missing_docs)]
pub mod common {
    pub mod v1 {
        tonic::include_proto!("racelog.common.v1");
    }
}

#[allow(missing_docs)]
pub mod track {
    pub mod v1 {
        tonic::include_proto!("racelog.track.v1");
    }
}

#[allow(missing_docs)]
pub mod event {
    pub mod v1 {
        tonic::include_proto!("racelog.event.v1");
    }
}

#[allow(missing_docs)]
pub mod provider {
    pub mod v1 {
        tonic::include_proto!("racelog.provider.v1");
    }
}

#[allow(missing_docs)]
pub mod racestate {
    pub mod v1 {
        tonic::include_proto!("racelog.racestate.v1");
    }
}
