#[tokio::main]
async fn main() {
    stock_pulse_lib::init_tracing();

    if let Err(error) = stock_pulse_lib::run().await {
        tracing::error!(%error, "stock-pulse exited with an error");
        std::process::exit(1);
    }
}
