use crate::error::{EntityError, Result};
use crate::model::{validity_overlaps, Price};
use crate::mutation::UpsertPriceMutation;

/// Gate applied before a price upsert is admitted anywhere: no other live
/// price may share `(price_list, currency, inner_record_id)` under a
/// different `price_id` while its validity overlaps the candidate's.
/// An absent validity is "always valid" and overlaps everything.
///
/// The caller supplies every live price currently known (base snapshot plus
/// already-pending upserts).
pub fn assert_price_unambiguous<'a>(
    live_prices: impl IntoIterator<Item = &'a Price>,
    candidate: &UpsertPriceMutation,
) -> Result<()> {
    for price in live_prices {
        if price.key.price_list == candidate.key.price_list
            && price.key.currency == candidate.key.currency
            && price.inner_record_id == candidate.inner_record_id
            && price.key.price_id != candidate.key.price_id
            && validity_overlaps(price.validity.as_ref(), candidate.validity.as_ref())
        {
            log::debug!(
                "price upsert {} rejected: collides with {}",
                candidate.key,
                price.key
            );
            return Err(EntityError::AmbiguousPrice {
                existing: price.key.clone(),
                candidate: candidate.key.clone(),
            });
        }
    }
    Ok(())
}
