//! CLI command handlers. Each one builds requests from arguments and leaves
//! the pipeline itself to `scrapelite-executor`.

pub mod execute;
