use anyhow::Context;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = natter::Config::from_env().context("Invalid configuration")?;
    log::info!("Starting with the {:?} merge policy", config.merge);

    tokio::task::LocalSet::new()
        .run_until(natter::run(config))
        .await
}
