use lumen_view::app::{LumenViewApp, APP_TITLE};
use lumen_view::config::ViewerConfig;
use lumen_view::launch::parse_launch_request_from_args;

fn main() -> eframe::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (initial_request, initial_status) = match parse_launch_request_from_args(&cli_args) {
        Ok(request) => (Some(request).filter(|r| !r.is_empty()), None),
        Err(err) => {
            log::warn!("Launch args error: {err}");
            (None, Some(format!("Launch args error: {err}")))
        }
    };
    let config_path = initial_request
        .as_ref()
        .and_then(|request| request.config.clone());
    let config = ViewerConfig::load_or_default(config_path.as_deref());

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_title(APP_TITLE)
            .with_inner_size([1280.0, 820.0])
            .with_resizable(true),
        ..Default::default()
    };

    eframe::run_native(
        APP_TITLE,
        native_options,
        Box::new(move |_cc| {
            Ok(Box::new(LumenViewApp::new(
                config,
                initial_request,
                initial_status,
            )))
        }),
    )
}
