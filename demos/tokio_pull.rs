#[cfg(feature = "async")]
mod enabled {
    use std::time::Duration;

    use wsman::AsyncClient;

    #[tokio::main(flavor = "current_thread")]
    pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
        // Example:
        //   cargo run --example tokio_pull --features async -- 192.168.1.20:16992 admin password CIM_Processor
        let mut args = std::env::args().skip(1);
        let target = args.next().ok_or("missing <host:port>")?.parse()?;
        let username = args.next().ok_or("missing <username>")?;
        let password = args.next().ok_or("missing <password>")?;
        let class = args.next().unwrap_or_else(|| "CIM_Processor".to_string());

        let client = AsyncClient::builder(target)
            .username(username)
            .password(password)
            .timeout(Duration::from_secs(5))
            .build()?;

        let exchange = client.call(&class, "Pull").await?;
        let envelope = exchange.envelope()?;
        println!("{}", serde_json::to_string_pretty(envelope.pull_items()?)?);

        Ok(())
    }
}

#[cfg(feature = "async")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    enabled::main()
}

#[cfg(not(feature = "async"))]
fn main() {
    eprintln!("This example requires feature `async` (or `tokio`).");
}
