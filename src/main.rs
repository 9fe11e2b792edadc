use std::sync::Arc;

use quill::config::{ApiConfig, SessionConfig};
use quill::http::HttpCommentApi;
use quill::models::Id;
use quill::render::{renderer_for, to_text, RenderMode, RenderOptions};
use quill::{SessionController, SortKey};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let mut args = std::env::args().skip(1);
    let subject_id: Id = match args.next().map(|a| a.parse()) {
        Some(Ok(id)) => id,
        _ => {
            eprintln!("usage: quill <subject-id> [newest|oldest|popular] [search term]");
            std::process::exit(2);
        }
    };
    let sort: SortKey = match args.next() {
        Some(s) => s.parse().map_err(anyhow::Error::msg)?,
        None => SortKey::default(),
    };
    let term = args.collect::<Vec<_>>().join(" ");

    let api_cfg = ApiConfig::from_env()?;
    info!("Comment backend: {}", api_cfg.base_url);
    let api = HttpCommentApi::new(api_cfg);

    let mut session = SessionController::new(Arc::new(api), SessionConfig::from_env());
    session.open(subject_id, None, None).await?;
    session.sort(sort);
    session.search(&term);

    let lines = renderer_for(RenderMode::Basic).render(session.forest(), &RenderOptions::default());
    print!("{}", to_text(&lines));
    if session.has_more() {
        println!("(more comments available)");
    }
    info!("{} comments loaded", session.total_count());
    session.close();
    Ok(())
}
