use std::env;
use std::time::Duration;

use chrono::{Local, TimeDelta};
use max_portal::{MaxSession, Portal};

#[tokio::main]
async fn main() -> max_portal::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let user = args.get(1).expect("usage: cube_state <user> [--boost <room>]");
    let password = env::var("MAX_PORTAL_PASSWORD").expect("MAX_PORTAL_PASSWORD not set");
    let boost = args
        .iter()
        .position(|a| a == "--boost")
        .and_then(|i| args.get(i + 1));

    let url = env::var("MAX_PORTAL_URL").unwrap_or_else(|_| Portal::Eq3.base_url().to_string());
    let mut session = MaxSession::builder(url)
        .timeout(Duration::from_secs(30))
        .build()?;

    println!("Logging in as {user}...");
    session.login(user, &password).await?;

    let state = session.get_state().await?;
    for room in &state.rooms {
        println!(
            "[{}] actual: {:?} | set point: {:?} | eco/comfort: {:?}/{:?}",
            room.name,
            room.actual_temperature,
            room.set_point_temperature,
            room.eco_temperature,
            room.comfort_temperature,
        );
        for device in &room.devices {
            println!(
                "    {} ({}){}",
                device.name,
                device.radio_address,
                if device.battery_low { " | BATTERY LOW" } else { "" },
            );
        }
    }

    if let Some(name) = boost {
        let room = state
            .room_by_name(name)
            .unwrap_or_else(|| panic!("no room named {name}"));
        let temperature = room.comfort_temperature.unwrap_or(21.0);
        let until = Local::now() + TimeDelta::hours(1);
        session
            .set_room_temporary_mode(room, temperature, until)
            .await?;
        println!("{name}: {temperature} until about {}", until.format("%H:%M"));
    }

    Ok(())
}
