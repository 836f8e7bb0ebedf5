use log::error;

use goodwe_udp::options::Options;

#[tokio::main]
async fn main() {
    if let Err(e) = goodwe_udp::app(Options::new()).await {
        error!("{:#}", e);
        eprintln!("{:#}", e);
        std::process::exit(255);
    }
}
