use stage_ngin::{StageConfig, flow};

fn main() -> anyhow::Result<()> {
    let mut config = StageConfig::default();
    if let Some(url) = std::env::args().nth(1) {
        config = config.with_asset_url(url);
    }
    flow::run(config)
}
