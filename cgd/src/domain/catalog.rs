//! Built-in whitelists used when a tenant's lists cannot be fetched

use super::filter::Whitelists;

/// Contact properties every tenant has
pub const BASE_CONTACT_PROPERTIES: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "mobile_phone_number",
    "city",
    "state",
    "postal_code",
    "country",
    "birth_date",
    "gender",
    "marketing_email_subscribed",
    "marketing_text_message_subscribed",
    "active_membership",
];

/// Interaction types the platform tracks
pub const INTERACTION_TYPES: &[&str] = &[
    "added_to_cart",
    "booked_appointment",
    "browsed_availability",
    "called_business",
    "claimed_referral_offer",
    "clicked_link",
    "confirmed_appointment",
    "contact_created",
    "contact_updated",
    "deactivated_vehicle",
    "delivered_email",
    "delivered_text_message",
    "dismissed_recommendation",
    "disqualified_for_automation",
    "excluded_from_automation",
    "expressed_future_interest",
    "opened_email",
    "purchased",
    "qualified_for_automation",
    "referred_customer",
    "removed_from_cart",
    "requested_appointment",
    "scheduled_future_reminder",
    "shared_referral_link",
    "spam_report",
    "submitted_feedback",
    "submitted_lead_capture",
    "subscribed_marketing_emails",
    "subscribed_marketing_text_messages",
    "subscribed_transactional_emails",
    "subscribed_transactional_text_messages",
    "undeliverable_email",
    "unexcluded_from_automation",
    "unsubscribed_all_emails",
    "unsubscribed_all_text_messages",
    "unsubscribed_from_this_offer",
    "unsubscribed_marketing_emails",
    "unsubscribed_marketing_text_messages",
    "unsubscribed_transactional_emails",
    "unsubscribed_transactional_text_messages",
    "updated_preference",
    "viewed_map",
    "viewed_my_appointments",
    "viewed_package_or_membership",
    "viewed_referral_claim_form",
    "viewed_referral_program",
    "viewed_website_after_booking",
    "visited",
    "visited_profile_link",
    "visited_website",
];

/// Whitelists built from the catalogues above
pub fn default_whitelists() -> Whitelists {
    Whitelists {
        attributes: BASE_CONTACT_PROPERTIES.iter().map(|s| s.to_string()).collect(),
        event_types: INTERACTION_TYPES.iter().map(|s| s.to_string()).collect(),
    }
}
