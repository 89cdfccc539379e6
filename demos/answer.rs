use sip::{Account, Client, Event, EventKind};
use tokio::signal::ctrl_c;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let client = Client::builder(Account::new("bob", "example.org").with_password("hunter2"))
        .max_calls(1)
        .build()?;

    // Answer every incoming call right away
    client.subscribe(EventKind::CallIncoming, {
        let client = client.clone();

        move |event| {
            let Event::CallIncoming {
                call,
                remote,
                display_name,
            } = event
            else {
                return;
            };

            println!("call from {} <{remote}>", display_name.as_deref().unwrap_or("unknown"));

            if let Some(call) = client.call(*call) {
                if let Err(e) = call.answer() {
                    eprintln!("failed to answer, {e}");
                }
            }
        }
    });

    client.subscribe(EventKind::CallDtmfStart, |event| println!("{event:?}"));
    client.subscribe(EventKind::CallClosed, |event| println!("{event:?}"));

    client.start().await?;

    ctrl_c().await?;

    client.stop().await?;

    Ok(())
}
