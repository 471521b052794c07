use anyhow::Result;

fn main() -> Result<()> {
    log_sift::run()
}
