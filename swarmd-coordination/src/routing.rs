//! Work-type routing for intelligent claims
//!
//! Routing is deterministic: `(work_type, priority)` picks a candidate
//! team, then the best agent within it. Specialist teams win over the
//! caller's team; within a team the least-loaded active agent is chosen,
//! ties broken by oldest heartbeat so idle agents rotate fairly.

use swarmd_core::types::AgentStatus;

/// Candidate team for a work type: the team whose agents are specialized
/// in exactly this work type, if any are registered, otherwise the team
/// the caller asked for.
pub fn candidate_team<'a>(agents: &'a [AgentStatus], work_type: &str, requested_team: &'a str) -> &'a str {
    agents
        .iter()
        .find(|agent| agent.specialization == work_type)
        .map(|agent| agent.team.as_str())
        .unwrap_or(requested_team)
}

/// Pick the claimant for a new work item. Returns the index into
/// `agents`, or `None` when no agent in the candidate team can claim.
pub fn select_agent(agents: &[AgentStatus], work_type: &str, requested_team: &str) -> Option<usize> {
    let team = candidate_team(agents, work_type, requested_team);
    agents
        .iter()
        .enumerate()
        .filter(|(_, agent)| agent.team == team && agent.can_claim())
        .min_by(|(_, a), (_, b)| {
            a.current_workload
                .cmp(&b.current_workload)
                .then(a.last_heartbeat.cmp(&b.last_heartbeat))
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use swarmd_core::types::{AgentState, PerformanceMetrics};

    fn agent(id: &str, team: &str, specialization: &str, workload: u32, heartbeat_age_secs: i64) -> AgentStatus {
        AgentStatus {
            agent_id: id.to_string(),
            team: team.to_string(),
            status: AgentState::Active,
            capacity: 5,
            current_workload: workload,
            last_heartbeat: Utc::now() - Duration::seconds(heartbeat_age_secs),
            specialization: specialization.to_string(),
            performance_metrics: PerformanceMetrics::default(),
        }
    }

    #[test]
    fn test_lowest_workload_wins() {
        let agents = vec![
            agent("agent_1", "core", "general", 3, 0),
            agent("agent_2", "core", "general", 1, 0),
        ];
        assert_eq!(select_agent(&agents, "perf_opt", "core"), Some(1));
    }

    #[test]
    fn test_tie_broken_by_oldest_heartbeat() {
        let agents = vec![
            agent("agent_1", "core", "general", 1, 5),
            agent("agent_2", "core", "general", 1, 60),
        ];
        assert_eq!(select_agent(&agents, "perf_opt", "core"), Some(1));
    }

    #[test]
    fn test_specialist_team_overrides_requested() {
        let agents = vec![
            agent("agent_1", "core", "general", 0, 0),
            agent("agent_2", "perf", "perf_opt", 2, 0),
        ];
        // a registered perf_opt specialist routes the work to team perf
        assert_eq!(select_agent(&agents, "perf_opt", "core"), Some(1));
    }

    #[test]
    fn test_no_candidate_when_team_saturated() {
        let mut saturated = agent("agent_1", "core", "general", 5, 0);
        saturated.capacity = 5;
        let mut draining = agent("agent_2", "core", "general", 0, 0);
        draining.status = AgentState::Draining;
        let agents = vec![saturated, draining];
        assert_eq!(select_agent(&agents, "perf_opt", "core"), None);
    }

    #[test]
    fn test_unknown_team_has_no_candidate() {
        let agents = vec![agent("agent_1", "core", "general", 0, 0)];
        assert_eq!(select_agent(&agents, "perf_opt", "qa"), None);
    }
}
