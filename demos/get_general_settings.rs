use std::time::Duration;

use wsman::{Client, Request};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example:
    //   cargo run --example get_general_settings -- 192.168.1.20:16992 admin password
    let mut args = std::env::args().skip(1);
    let target = args.next().ok_or("missing <host:port>")?.parse()?;
    let username = args.next().ok_or("missing <username>")?;
    let password = args.next().ok_or("missing <password>")?;

    let client = Client::builder(target)
        .username(username)
        .password(password)
        .timeout(Duration::from_secs(5))
        .retries(3)
        .build()?;

    let exchange = client.send(Request::new("AMT_GeneralSettings", "Get"))?;
    let settings = exchange.envelope()?.payload()?;
    println!("{}", serde_json::to_string_pretty(&settings)?);

    let uuid = client.call("AMT_SetupAndConfigurationService", "GetUuid")?;
    if let Some(uuid) = uuid.envelope()?.uuid() {
        println!("UUID: {uuid}");
    }

    Ok(())
}
