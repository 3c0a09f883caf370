//! Auto-response template selection
//!
//! The reply text for a missed call is a fixed template keyed by the
//! business's subscription tier. The tier is a closed enum and every
//! response-generation site matches it exhaustively.

use crate::types::SubscriptionTier;

/// Render the auto-response body for a missed call.
pub fn auto_response_body(
    tier: SubscriptionTier,
    business_name: &str,
    customer_name: Option<&str>,
) -> String {
    match tier {
        SubscriptionTier::Basic => format!(
            "Hi! You've reached {business_name}. Sorry we missed your call — reply to this text and we'll get right back to you."
        ),
        SubscriptionTier::Pro => {
            let greeting = match customer_name {
                Some(name) => format!("Hi {name}!"),
                None => "Hi!".to_string(),
            };
            format!(
                "{greeting} Thanks for calling {business_name}. We couldn't pick up just now — text us here and a team member will reply shortly."
            )
        }
        SubscriptionTier::Enterprise => {
            let greeting = match customer_name {
                Some(name) => format!("Hi {name},"),
                None => "Hi,".to_string(),
            };
            format!(
                "{greeting} thank you for calling {business_name}. Your call matters to us — reply to this message and a dedicated team member will respond right away, or we'll call you back as soon as a line frees up."
            )
        }
    }
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;

        #[test]
        fn test_every_tier_names_the_business() {
            for tier in [
                SubscriptionTier::Basic,
                SubscriptionTier::Pro,
                SubscriptionTier::Enterprise,
            ] {
                let body = auto_response_body(tier, "Ada's Bakery", None);
                assert!(body.contains("Ada's Bakery"), "{tier:?}: {body}");
            }
        }

        #[test]
        fn test_pro_and_enterprise_greet_known_customers() {
            let pro = auto_response_body(SubscriptionTier::Pro, "Ada's Bakery", Some("Grace"));
            assert!(pro.starts_with("Hi Grace!"));

            let enterprise =
                auto_response_body(SubscriptionTier::Enterprise, "Ada's Bakery", Some("Grace"));
            assert!(enterprise.starts_with("Hi Grace,"));
        }

        #[test]
        fn test_basic_ignores_customer_name() {
            let with_name = auto_response_body(SubscriptionTier::Basic, "Shop", Some("Grace"));
            let without = auto_response_body(SubscriptionTier::Basic, "Shop", None);
            assert_eq!(with_name, without);
        }
    }
}
