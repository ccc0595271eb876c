use ethers::types::U256;
use log::info;

use super::{check_supply, sort_allocations, Allocation};
use crate::error::AllocationError;
use crate::holders::CombinedHolder;
use crate::normalization::{display_tokens, mul_div_floor};

/// Splits `supply` pro rata over the total GNO of every eligible holder.
#[derive(Debug, Clone)]
pub struct HolderAllocator {
    supply: U256,
}

impl HolderAllocator {
    pub fn new(supply: U256) -> Self {
        Self { supply }
    }

    /// `supply * total_amount // eligible_supply` per holder, sorted by
    /// descending amount.
    pub fn allocate(&self, holders: &[CombinedHolder]) -> Result<Vec<Allocation>, AllocationError> {
        let eligible_supply = holders.iter().try_fold(U256::zero(), |acc, h| {
            acc.checked_add(h.total_amount)
                .ok_or(AllocationError::Overflow("eligible holder supply"))
        })?;
        if eligible_supply.is_zero() {
            info!("no eligible holder supply, nothing to allocate");
            return Ok(Vec::new());
        }
        info!(
            "allocating holder supply over {} GNO held by {} accounts",
            display_tokens(eligible_supply),
            holders.len()
        );

        let mut allocations = holders
            .iter()
            .map(|h| {
                Ok(Allocation::new(
                    h.account.clone(),
                    mul_div_floor(self.supply, h.total_amount, eligible_supply)?,
                ))
            })
            .collect::<Result<Vec<_>, AllocationError>>()?;
        check_supply("holder", &allocations, self.supply)?;
        sort_allocations(&mut allocations);
        Ok(allocations)
    }
}
