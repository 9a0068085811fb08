//! Console host for the broadcaster.
//!
//! Usage: `broadcaster [ROUTE]`, where ROUTE defaults to
//! `/live?broadcaster=true`.

fn main() -> anyhow::Result<()> {
    broadcaster_lib::run()
}
