use anyhow::Result;

fn main() -> Result<()> {
    clipy::cli::run()
}
