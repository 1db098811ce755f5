use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[command(name = "arbord", version, about = "Arbor Network blockchain daemon")]
pub struct NodeConfig {
    /// Directory holding the chain database
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Keep the database in memory only, nothing touches disk
    #[arg(long)]
    pub in_memory: bool,

    /// Chain identifier as 32 bytes of hex, all zero by default
    #[arg(long)]
    pub chain_id: Option<String>,

    /// Consensus engine to run: solo or bft
    #[arg(long, default_value = "solo")]
    pub engine: String,

    /// Produce blocks with this hex-encoded secret key
    #[arg(long)]
    pub leader_key: Option<String>,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
