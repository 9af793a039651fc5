fn main() {
    if let Err(err) = sightings_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
