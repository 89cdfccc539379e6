use sip::{Account, Client, Event};
use tokio::select;
use tokio::signal::ctrl_c;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let client = Client::builder(Account::new("bob", "example.org").with_password("hunter2"))
        .build()?;

    let mut events = client.subscribe_channel();

    client.start().await?;

    // Call alice
    let call = client.make_call("alice@example.org")?;

    loop {
        let event = select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = ctrl_c() => {
                // Cancels the call if it was not answered yet
                call.hangup(None, None)?;
                continue;
            }
        };

        if event.call() != Some(call.id()) {
            continue;
        }

        match event {
            Event::CallEstablished { .. } => {
                println!("alice answered");

                // Tell alice who is calling
                for digit in "1234#".chars() {
                    call.send_dtmf(digit)?;
                }
            }
            Event::CallClosed { reason, .. } => {
                println!("call ended: {reason:?}");
                break;
            }
            event => println!("{event:?}"),
        }
    }

    client.stop().await?;

    Ok(())
}
