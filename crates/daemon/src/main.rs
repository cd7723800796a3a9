#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Some(arg) = std::env::args().nth(1) {
        if matches!(arg.as_str(), "version" | "--version" | "-v") {
            println!("{}", tinyserved::version::long());
            return Ok(());
        }
    }

    tinyserved::init_tracing();
    let config = tinyserved::config::load()?;
    tracing::info!(
        version = tinyserved::version::VERSION,
        commit = tinyserved::version::COMMIT,
        data_dir = %config.data_dir.display(),
        "tinyserved starting"
    );
    tinyserved::run(config).await
}
