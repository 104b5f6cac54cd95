fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = "proto";

    // Only the client half of ADS is used.
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(
            &[
                "proto/envoy/api/v2/cds.proto",
                "proto/envoy/api/v2/eds.proto",
                "proto/envoy/api/v2/discovery.proto",
                "proto/envoy/service/discovery/v2/ads.proto",
            ],
            &[proto_dir],
        )?;

    Ok(())
}
