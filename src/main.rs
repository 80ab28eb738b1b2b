use log::error;

#[tokio::main]
async fn main() {
    if let Err(err) = smh_bridge::app().await {
        error!("{:?}", err);
        std::process::exit(1);
    }
}
