fn main() -> anyhow::Result<()> {
    scrapelite::run_cli()
}
