use influx_proxy::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    influx_proxy::run().await
}
