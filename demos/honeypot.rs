use ipmi_honeypot::{PrivilegeLevel, ServerConfig, User};

// Example:
//   cargo run --example honeypot -- 0.0.0.0:623 rack-7-bmc
//   cargo run --example honeypot --features async -- 0.0.0.0:623 rack-7-bmc
fn config() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let bind = args
        .next()
        .unwrap_or_else(|| "0.0.0.0:623".to_owned())
        .parse()?;
    let device_name = args.next().unwrap_or_else(|| "BMC".to_owned());

    Ok(ServerConfig::builder()
        .bind(bind)
        .device_name(device_name)
        .user("ADMIN", "ADMIN", PrivilegeLevel::Administrator)
        .user_entry(User::new("root", "calvin", PrivilegeLevel::Administrator).fixed(true))
        .user("operator", "operator", PrivilegeLevel::Operator)
        .build()?)
}

#[cfg(feature = "async")]
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let server = ipmi_honeypot::TokioUdpServer::bind(config()?).await?;
    eprintln!("listening on {}", server.local_addr()?);
    server.run().await?;
    Ok(())
}

#[cfg(all(feature = "blocking", not(feature = "async")))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut server = ipmi_honeypot::UdpServer::bind(config()?)?;
    eprintln!("listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}

#[cfg(not(any(feature = "blocking", feature = "async")))]
fn main() {
    let _ = config;
    eprintln!("This example requires feature `blocking` or `async`.");
}
