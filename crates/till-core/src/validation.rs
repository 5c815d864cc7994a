//! Payload validation: structural checks run before anything is written.
//!
//! The server has the final say (it may still reject a payload), but a
//! payload that fails these checks can never succeed, so it is refused at
//! the register instead of sitting in the log.

use crate::entity::SaleItem;
use crate::error::ValidationError;
use crate::mutation::MutationPayload;
use crate::types::EntityId;

/// Validate a mutation payload.
///
/// This performs:
/// - Non-empty ids
/// - At least one item for sales and returns
/// - Positive quantities and non-negative prices
/// - Sale total equals the sum of line totals
/// - Non-zero inventory deltas
pub fn validate_payload(payload: &MutationPayload) -> Result<(), ValidationError> {
    match payload {
        MutationPayload::Sale {
            sale_id,
            items,
            total_cents,
            ..
        } => {
            check_id(sale_id)?;
            check_items("sale", items)?;
            let expected: i64 = items.iter().map(SaleItem::line_total_cents).sum();
            if *total_cents != expected {
                return Err(ValidationError::TotalMismatch {
                    total: *total_cents,
                    expected,
                });
            }
            Ok(())
        }
        MutationPayload::Return {
            return_id,
            sale_id,
            items,
            ..
        } => {
            check_id(return_id)?;
            check_id(sale_id)?;
            check_items("return", items)
        }
        MutationPayload::InventoryAdjustment {
            product_id, delta, ..
        } => {
            check_id(product_id)?;
            if *delta == 0 {
                return Err(ValidationError::ZeroDelta);
            }
            Ok(())
        }
    }
}

fn check_id(id: &EntityId) -> Result<(), ValidationError> {
    if id.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(())
}

fn check_items(what: &'static str, items: &[SaleItem]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::NoItems(what));
    }
    for (index, item) in items.iter().enumerate() {
        check_id(&item.product_id)?;
        if item.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity {
                index,
                quantity: item.quantity,
            });
        }
        if item.unit_price_cents < 0 {
            return Err(ValidationError::NegativePrice {
                index,
                price: item.unit_price_cents,
            });
        }
    }
    Ok(())
}
