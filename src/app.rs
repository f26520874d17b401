use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api;
use crate::config;
use crate::data::{ApiDetailService, DetailService};
use crate::feed::{Feed, FeedOptions};
use crate::logging;
use crate::mpv::{MpvBackend, MpvOptions};
use crate::route::Location;
use crate::ui;
use crate::view::LayoutKind;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    /// Starting location; any route form, or a full URL.
    pub location: Option<String>,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    logging::init().context("init logging")?;

    let config_path = options.config_file.clone().or_else(config::default_path);
    tracing::info!(config = %friendly_path(config_path.as_ref()), "configuration loaded");

    let client = api::Client::new(api::ClientConfig {
        base_url: cfg.api.base_url.clone(),
        user_agent: cfg.api.user_agent.clone(),
        timeout: Some(cfg.api.timeout),
        http_client: None,
    })
    .context("create api client")?;
    let service: Arc<dyn DetailService> = Arc::new(ApiDetailService::new(Arc::new(client)));

    let backend = MpvBackend::new(MpvOptions {
        mpv_path: cfg.player.mpv_path.clone(),
        fullscreen: cfg.player.fullscreen,
        user_agent: cfg.api.user_agent.clone(),
        referer: cfg.player.referer.clone(),
        extra_args: cfg.player.extra_args.clone(),
    });

    let (width, _) = crossterm::terminal::size().context("query terminal size")?;
    let layout = LayoutKind::for_width(width, cfg.ui.mobile_max_width);

    let location = options
        .location
        .map(Location::new)
        .unwrap_or_else(Location::root);

    let mut feed = Feed::new(FeedOptions {
        service,
        backend: Box::new(backend),
        config: cfg,
        layout,
    });
    feed.mount(location);

    let mut app = ui::App::new(feed);
    app.run()
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/reels-tui/config.yaml".to_string()
    }
}
