use abr_player::args::{get_log_level_filter, parse_args};
use abr_player::utils::{create_metrics, start_metrics_server};
use abr_player::PlayerSession;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[tokio::main]
async fn main() {
    let args = parse_args();

    // Build the FmtSubscriber layer
    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(get_log_level_filter(&args));

    #[cfg(feature = "console-tracing")]
    let subscriber = {
        let console_layer = console_subscriber::ConsoleLayer::builder()
            .retention(std::time::Duration::from_secs(60))
            .server_addr(([127, 0, 0, 1], 5555))
            .spawn();
        tracing_subscriber::registry().with(console_layer).with(fmt_layer)
    };

    #[cfg(not(feature = "console-tracing"))]
    let subscriber = tracing_subscriber::registry().with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global default subscriber");

    info!("Starting headless playback client");
    info!("{:?}", args);

    create_metrics().unwrap();
    start_metrics_server(args.port);

    let config = args.to_config();
    let session = match PlayerSession::new(config) {
        Ok(session) => session,
        Err(e) => {
            error!("failed to set up the playback session: {e}");
            std::process::exit(1);
        }
    };

    match session.run().await {
        Ok(report) => {
            let mut out = std::io::stdout();
            if let Err(e) = session.analyzer().save(&mut out) {
                error!("failed to write the analysis: {e}");
            }
            if args.dump_json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => error!("failed to serialize the report: {e}"),
                }
            }
        }
        Err(e) => {
            error!("playback failed: {e}");
            std::process::exit(1);
        }
    }
}
