//! Structured logging init (spec ambient stack), mirroring the teacher's
//! `init_tracing`: an `EnvFilter` defaulting to `info`, compact output by
//! default with JSON available via `RT_LOG_FORMAT=json`.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,rt_runtime=debug"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("RT_LOG_FORMAT").as_deref() == Ok("json") {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }
}
