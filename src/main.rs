use anyhow::Result;

fn main() -> Result<()> {
    env_logger::init();
    let matches = emsbus::cli::parse_args();
    emsbus::cli::actions::run(&matches)
}
