use sip::{Account, Client, EventKind};
use std::time::Duration;
use tokio::signal::ctrl_c;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Credentials for bob
    let account = Account::new("bob", "example.org")
        .with_password("hunter2")
        .with_registration_interval(Duration::from_secs(600));

    let client = Client::builder(account)
        .on(EventKind::DidRegister, |event| println!("registered: {event:?}"))
        .on(EventKind::FailedRegister, |event| println!("failed: {event:?}"))
        .build()?;

    // Opens the transport and sends the first REGISTER
    client.start().await?;

    ctrl_c().await?;

    // unregister bob
    client.stop().await?;

    Ok(())
}
