fn main() {
    if let Err(err) = landing_analytics_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
