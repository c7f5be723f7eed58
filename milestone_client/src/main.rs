use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use milestone_client::ProofTracker;
use milestone_core::record::ProofStatus;

const USAGE: &str = "usage: milestone_client <health | list <campaignId> | \
submit <campaignId> <index> <content> [submitter] | \
status <campaignId> <index> <pending|confirmed|rejected> [txHash] | \
delete <campaignId> <index>>";

fn index_arg(raw: Option<&String>) -> Result<u32> {
    let raw = raw.context(USAGE)?;
    raw.parse()
        .with_context(|| format!("milestone index must be a number, got '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let base_url =
        std::env::var("PROOF_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let tracker = ProofTracker::new(base_url);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    match command.as_str() {
        "health" => {
            let health = tracker.health_check().await?;
            println!("{health:#?}");
        }
        "list" => {
            let campaign = args.get(1).context(USAGE)?;
            let proofs = tracker.get_campaign_proofs(campaign).await?;
            println!("{}", serde_json::to_string_pretty(&proofs)?);
        }
        "submit" => {
            let campaign = args.get(1).context(USAGE)?;
            let index = index_arg(args.get(2))?;
            let content = args.get(3).context(USAGE)?;
            let submitter = args.get(4).map(String::as_str);
            let proof = tracker
                .save_proof(campaign, index, content, submitter)
                .await?;
            println!("{}", serde_json::to_string_pretty(&proof)?);
        }
        "status" => {
            let campaign = args.get(1).context(USAGE)?;
            let index = index_arg(args.get(2))?;
            let status: ProofStatus = args
                .get(3)
                .context(USAGE)?
                .parse()
                .map_err(anyhow::Error::msg)?;
            let tx_hash = args.get(4).map(String::as_str);
            let proof = tracker
                .update_milestone_proof_status(campaign, index, status, tx_hash)
                .await?;
            println!("{}", serde_json::to_string_pretty(&proof)?);
        }
        "delete" => {
            let campaign = args.get(1).context(USAGE)?;
            let index = index_arg(args.get(2))?;
            if tracker.delete_proof(campaign, index).await? {
                println!("deleted proof for {campaign}#{index}");
            } else {
                println!("no proof stored for {campaign}#{index}");
            }
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }

    Ok(())
}
