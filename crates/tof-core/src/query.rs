//! Predicate + sort + pagination evaluation shared by every listing path.
//!
//! Predicates are conjunctive; every sort breaks ties by id ascending so a
//! repeated query over unchanged data returns identical pages.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Intent, Opportunity, ParseEnumError, RecommendedAction, Thread};

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            _ => Err(ParseEnumError {
                kind: "sort order",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec<F> {
    pub field: F,
    pub order: SortOrder,
}

impl<F: Default> Default for SortSpec<F> {
    fn default() -> Self {
        Self {
            field: F::default(),
            order: SortOrder::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: usize,
    pub offset: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl PageRequest {
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// One page of results plus the unpaged total for the same predicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

pub trait Queryable {
    type Filter;
    type SortField: Copy;

    fn id(&self) -> Uuid;
    fn matches(&self, filter: &Self::Filter) -> bool;
    fn compare_by(&self, other: &Self, field: Self::SortField) -> Ordering;
}

fn ordered<T: Queryable>(a: &T, b: &T, sort: &SortSpec<T::SortField>) -> Ordering {
    let by_field = a.compare_by(b, sort.field);
    let by_field = match sort.order {
        SortOrder::Asc => by_field,
        SortOrder::Desc => by_field.reverse(),
    };
    by_field.then_with(|| a.id().cmp(&b.id()))
}

/// Filter, sort and paginate `items`.
pub fn run_query<T: Queryable>(
    items: impl IntoIterator<Item = T>,
    filter: &T::Filter,
    sort: &SortSpec<T::SortField>,
    page: PageRequest,
) -> Page<T> {
    let mut matched = items
        .into_iter()
        .filter(|item| item.matches(filter))
        .collect::<Vec<_>>();
    matched.sort_by(|a, b| ordered(a, b, sort));
    let total = matched.len();
    let items = matched
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .collect();
    Page {
        items,
        total,
        limit: page.limit,
        offset: page.offset,
    }
}

pub fn count_matching<'a, T: Queryable + 'a>(
    items: impl IntoIterator<Item = &'a T>,
    filter: &T::Filter,
) -> usize {
    items.into_iter().filter(|item| item.matches(filter)).count()
}

fn text_matches(needle: &Option<String>, title: &str, body: &str) -> bool {
    let Some(needle) = needle.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
        return true;
    };
    let needle = needle.to_lowercase();
    title.to_lowercase().contains(&needle) || body.to_lowercase().contains(&needle)
}

fn eq_if_set<T: PartialEq>(wanted: &Option<T>, actual: &T) -> bool {
    wanted.as_ref().map_or(true, |w| w == actual)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadFilter {
    pub source: Option<String>,
    pub intent: Option<Intent>,
    pub search: Option<String>,
    pub thread_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSortField {
    #[default]
    CrawledAt,
    Upvotes,
    Title,
    Source,
}

impl FromStr for ThreadSortField {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crawled_at" => Ok(Self::CrawledAt),
            "upvotes" => Ok(Self::Upvotes),
            "title" => Ok(Self::Title),
            "source" => Ok(Self::Source),
            _ => Err(ParseEnumError {
                kind: "thread sort field",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadQuery {
    pub filter: ThreadFilter,
    pub sort: SortSpec<ThreadSortField>,
    pub page: PageRequest,
}

impl Queryable for Thread {
    type Filter = ThreadFilter;
    type SortField = ThreadSortField;

    fn id(&self) -> Uuid {
        self.id
    }

    fn matches(&self, filter: &ThreadFilter) -> bool {
        filter
            .source
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case(&self.source))
            && eq_if_set(&filter.intent, &self.intent)
            && eq_if_set(&filter.thread_id, &self.id)
            && text_matches(&filter.search, &self.title, &self.body)
    }

    fn compare_by(&self, other: &Self, field: ThreadSortField) -> Ordering {
        match field {
            ThreadSortField::CrawledAt => self.crawled_at.cmp(&other.crawled_at),
            ThreadSortField::Upvotes => self.upvotes.cmp(&other.upvotes),
            ThreadSortField::Title => self.title.cmp(&other.title),
            ThreadSortField::Source => self.source.cmp(&other.source),
        }
    }
}

/// An opportunity joined with the thread it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityListing {
    pub opportunity: Opportunity,
    pub thread: Thread,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    pub source: Option<String>,
    pub intent: Option<Intent>,
    pub score: Option<f64>,
    pub score_min: Option<f64>,
    pub score_max: Option<f64>,
    pub serp_match: Option<bool>,
    pub action: Option<RecommendedAction>,
    pub search: Option<String>,
    pub thread_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpportunitySortField {
    #[default]
    Score,
    ComputedAt,
    Upvotes,
    Title,
}

impl FromStr for OpportunitySortField {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" => Ok(Self::Score),
            "computed_at" => Ok(Self::ComputedAt),
            "upvotes" => Ok(Self::Upvotes),
            "title" => Ok(Self::Title),
            _ => Err(ParseEnumError {
                kind: "opportunity sort field",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpportunityQuery {
    pub filter: OpportunityFilter,
    pub sort: SortSpec<OpportunitySortField>,
    pub page: PageRequest,
}

impl Queryable for OpportunityListing {
    type Filter = OpportunityFilter;
    type SortField = OpportunitySortField;

    fn id(&self) -> Uuid {
        self.opportunity.id
    }

    fn matches(&self, filter: &OpportunityFilter) -> bool {
        let o = &self.opportunity;
        filter
            .source
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case(&self.thread.source))
            && eq_if_set(&filter.intent, &o.intent)
            && filter.score.map_or(true, |s| o.score == s)
            && filter.score_min.map_or(true, |min| o.score >= min)
            && filter.score_max.map_or(true, |max| o.score <= max)
            && eq_if_set(&filter.serp_match, &o.serp_match)
            && eq_if_set(&filter.action, &o.action)
            && eq_if_set(&filter.thread_id, &o.thread_id)
            && text_matches(&filter.search, &self.thread.title, &self.thread.body)
    }

    fn compare_by(&self, other: &Self, field: OpportunitySortField) -> Ordering {
        match field {
            OpportunitySortField::Score => self.opportunity.score.total_cmp(&other.opportunity.score),
            OpportunitySortField::ComputedAt => {
                self.opportunity.computed_at.cmp(&other.opportunity.computed_at)
            }
            OpportunitySortField::Upvotes => self.thread.upvotes.cmp(&other.thread.upvotes),
            OpportunitySortField::Title => self.thread.title.cmp(&other.thread.title),
        }
    }
}
