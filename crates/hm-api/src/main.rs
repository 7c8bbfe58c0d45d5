#[tokio::main]
async fn main() {
    if let Err(err) = hm_api::run().await {
        tracing::error!(error = %err, "hm-api failed");
        std::process::exit(1);
    }
}
