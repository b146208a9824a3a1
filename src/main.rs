fn main() -> anyhow::Result<()> {
    thoughtsync_lib::run()
}
