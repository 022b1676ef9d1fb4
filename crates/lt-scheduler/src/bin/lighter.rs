//! `lighter` with the built-in dry-run catalog.

fn main() -> anyhow::Result<()> {
    lt_scheduler::cli::run_with(lt_engine::builtin_catalog())
}
