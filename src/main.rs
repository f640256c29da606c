fn main() -> anyhow::Result<()> {
    physiolens_lib::run()
}
