//! Similar-ticket search.
//!
//! Builds the gateway search predicate from a ticket summary and runs the
//! two-tier policy: same company over a wide window first, then a global
//! search over a short window when the company alone turns up too little.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use deskmate_shared::{Lexicon, TicketRecord};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

use super::keywords::extract_keywords;
use crate::config::SearchConfig;
use crate::gateway::{timed, GatewayError, SearchOptions, TicketGateway};

/// Where a similarity search looks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    pub company_id: Option<i64>,
    pub exclude_id: Option<i64>,
    pub lookback_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarityQuery {
    pub keywords: Vec<String>,
    pub company_scope: Option<i64>,
    pub exclude_id: Option<i64>,
    pub since: DateTime<Utc>,
}

impl SimilarityQuery {
    /// Build a query, or None when the summary yields no keywords
    pub fn build(
        summary: &str,
        scope: &SearchScope,
        lexicon: &Lexicon,
        max_keywords: usize,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let keywords = extract_keywords(summary, lexicon, max_keywords);
        if keywords.is_empty() {
            return None;
        }
        Some(Self {
            keywords,
            company_scope: scope.company_id,
            exclude_id: scope.exclude_id,
            since: now - ChronoDuration::days(scope.lookback_days),
        })
    }

    /// Render as a gateway `conditions` expression
    pub fn conditions(&self) -> String {
        let mut clauses = vec![format!(
            "dateEntered >= [{}]",
            self.since.format("%Y-%m-%dT%H:%M:%SZ")
        )];
        if let Some(company) = self.company_scope {
            clauses.push(format!("company/id = {}", company));
        }
        if let Some(excluded) = self.exclude_id {
            clauses.push(format!("id != {}", excluded));
        }
        let any_keyword = self
            .keywords
            .iter()
            .map(|k| format!("summary contains \"{}\"", k.replace('"', "\\\"")))
            .collect::<Vec<_>>()
            .join(" OR ");
        clauses.push(format!("({})", any_keyword));
        clauses.join(" AND ")
    }
}

/// Closed-like tickets first, gateway order kept inside each group, then cap
pub fn rank_candidates(
    tickets: Vec<TicketRecord>,
    lexicon: &Lexicon,
    cap: usize,
) -> Vec<TicketRecord> {
    let (mut closed, open): (Vec<_>, Vec<_>) = tickets
        .into_iter()
        .partition(|t| lexicon.is_closed_status(t.status_name()));
    closed.extend(open);
    closed.truncate(cap);
    closed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTier {
    Tenant,
    Global,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarSearch {
    pub keywords: Vec<String>,
    /// Tiers in the order they were searched
    pub tiers: Vec<SearchTier>,
    /// Ranked and capped
    pub candidates: Vec<TicketRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimilarOutcome {
    /// Summary had nothing searchable; no search was issued
    NoKeywords,
    Searched(SimilarSearch),
}

impl SimilarOutcome {
    pub fn candidates(&self) -> &[TicketRecord] {
        match self {
            SimilarOutcome::NoKeywords => &[],
            SimilarOutcome::Searched(search) => &search.candidates,
        }
    }
}

/// Run the two-tier search for tickets resembling `target`
pub async fn find_similar(
    gateway: &dyn TicketGateway,
    target: &TicketRecord,
    policy: &SearchConfig,
    lexicon: &Lexicon,
    now: DateTime<Utc>,
    limit: Duration,
) -> Result<SimilarOutcome, GatewayError> {
    let summary = target.summary_text();
    let options = SearchOptions::similarity(policy.fetch_cap);
    let mut found: Vec<TicketRecord> = Vec::new();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut tiers = Vec::new();
    let mut keywords = Vec::new();

    let mut plan = Vec::new();
    if let Some(company) = target.company_id() {
        plan.push((SearchTier::Tenant, Some(company), policy.tenant_window_days));
    }
    plan.push((SearchTier::Global, None, policy.global_window_days));

    for (tier, company_id, lookback_days) in plan {
        if tier == SearchTier::Global && found.len() >= policy.min_tenant_matches {
            break;
        }
        let scope = SearchScope {
            company_id,
            exclude_id: Some(target.id),
            lookback_days,
        };
        let Some(query) =
            SimilarityQuery::build(summary, &scope, lexicon, policy.max_keywords, now)
        else {
            debug!("Ticket {} summary has no searchable keywords", target.id);
            return Ok(SimilarOutcome::NoKeywords);
        };
        keywords = query.keywords.clone();

        let conditions = query.conditions();
        debug!("Similarity search ({:?}): {}", tier, conditions);
        let results = timed(limit, gateway.search_tickets(&conditions, &options)).await?;
        tiers.push(tier);

        for ticket in results {
            if ticket.id != target.id && seen.insert(ticket.id) {
                found.push(ticket);
            }
        }
    }

    found.truncate(policy.fetch_cap);
    let candidates = rank_candidates(found, lexicon, policy.ranked_cap);
    info!(
        "Similar tickets for {}: {} candidates via {:?}",
        target.id,
        candidates.len(),
        tiers
    );
    Ok(SimilarOutcome::Searched(SimilarSearch {
        keywords,
        tiers,
        candidates,
    }))
}
