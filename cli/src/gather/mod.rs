use crate::GatherOptions;
use futures_util::StreamExt;
use icegather::network::os::OsNetwork;
use icegather::Agent;
use icegather::AgentConfig;
use icegather::Candidate;
use icegather::CandidateEvent;
use icegather::Nat1To1CandidateType;
use serde::Serialize;
use std::sync::Arc;

pub async fn gather(options: GatherOptions) -> anyhow::Result<()> {
    log::info!("Detecting network interfaces");
    let mut config = AgentConfig::new(Arc::new(OsNetwork::detect().await));
    config.network_types = options.network_types.into_iter().collect();
    if !options.interfaces.is_empty() {
        let interfaces = options.interfaces;
        config.interface_filter = Some(Arc::new(move |name: &str| {
            interfaces.iter().any(|i| i == name)
        }));
    }
    config.nat_1to1_ips = options.nat_1to1_ips;
    if options.nat_1to1_srflx {
        config.nat_1to1_candidate_type = Nat1To1CandidateType::ServerReflexive;
    }
    config.port_min = options.port_min;
    config.port_max = options.port_max;
    config.trickle = true;

    let agent = Agent::new(config)?;
    let mut events = agent.subscribe()?;
    agent.gather_candidates()?;

    let mut outcome = Ok(());
    while let Some(event) = events.next().await {
        match event {
            CandidateEvent::Discovered(candidate) => print(&candidate, options.json)?,
            CandidateEvent::Completed => break,
            CandidateEvent::Failed(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }
    agent.close()?;
    outcome
}

fn print(candidate: &Candidate, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(&CandidateRecord::from(candidate))?);
    } else {
        println!("{}", candidate);
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateRecord {
    id: String,
    foundation: String,
    priority: u32,
    component: u16,
    network_type: String,
    candidate_type: &'static str,
    address: String,
    port: u16,
    related_address: Option<String>,
}

impl From<&Candidate> for CandidateRecord {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id().into(),
            foundation: candidate.foundation().into(),
            priority: candidate.priority(),
            component: candidate.component(),
            network_type: candidate.network_type().to_string(),
            candidate_type: candidate.kind().as_str(),
            address: candidate.address().to_string(),
            port: candidate.port(),
            related_address: candidate.related_address().map(|a| a.to_string()),
        }
    }
}
