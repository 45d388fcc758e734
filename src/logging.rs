use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

pub fn init(configured: Option<&str>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(configured))
        .with_timer(LocalTimer)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter(configured: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        configured
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    })
}
