//! Core domain types: conversation state, phases, filter queries, tenants

pub mod catalog;
pub mod filter;
pub mod phase;
pub mod state;
pub mod tenant;

pub use catalog::default_whitelists;
pub use filter::{
    AttributeFilter, AttributeOp, EventFilter, EventOp, EventTypes, FilterQuery, FilterShapeError, MembershipOp,
    MetadataFilter, ParsedFilter, Predicate, SegmentMembershipFilter, UnknownNames, Whitelists,
};
pub use phase::Phase;
pub use state::{
    ALL_CUSTOMERS, AnsweredQuestion, BEST_JUDGMENT, CampaignBrief, ConversationState, MatchedSegment,
    default_segment_display_name,
};
pub use tenant::{Credentials, Location, TenantContext};
