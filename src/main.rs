#[tokio::main]
async fn main() {
    match vastctl::cli::run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            let rendered = serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string());
            eprintln!("{}", rendered);
            std::process::exit(1);
        }
    }
}
