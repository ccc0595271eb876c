// Uniswap V3 position valuation: exact integer port of TickMath / SqrtPriceMath
use ethers::types::{U256, U512};

use crate::error::AllocationError;
use crate::normalization::{mul_div_floor, mul_div_round_up};
use crate::types::conversions::u512_to_u256;
use crate::types::{Account, HolderRecord};

/// Uniswap V3 constants
pub const MIN_TICK: i32 = -887272;
pub const MAX_TICK: i32 = 887272;
pub const MIN_SQRT_RATIO: U256 = U256([4295128739, 0, 0, 0]); // sqrt(1.0001^-887272) * 2^96
pub const MAX_SQRT_RATIO: U256 = U256([6743328256752651558, 17280870778742802505, 4294805859, 0]); // sqrt(1.0001^887272) * 2^96

/// Q96 fixed point constants
pub const Q96: U256 = U256([0, 1 << 32, 0, 0]); // 2^96
const Q32_MASK: U256 = U256([0xffff_ffff, 0, 0, 0]);

/// `2^128 / sqrt(1.0001)` when bit 0 of |tick| is set.
const BIT0_RATIO: u128 = 0xfffcb933bd6fad37aa2d162d1a594001;

/// `2^128 / sqrt(1.0001)^(2^k)` for k = 1..=19, applied per set bit of |tick|.
const BIT_MULTIPLIERS: [u128; 19] = [
    0xfff97272373d413259a46990580e213a,
    0xfff2e50f5f656932ef12357cf3c7fdcc,
    0xffe5caca7e10e4e61c3624eaa0941cd0,
    0xffcb9843d60f6159c9db58835c926644,
    0xff973b41fa98c081472e6896dfb254c0,
    0xff2ea16466c96a3843ec78b326b52861,
    0xfe5dee046a99a2a811c461f1969c3053,
    0xfcbe86c7900a88aedcffc83b479aa3a4,
    0xf987a7253ac413176f2b074cf7815e54,
    0xf3392b0822b70005940c7a398e4b70f3,
    0xe7159475a2c29b7443b29c7fa6e889d9,
    0xd097f3bdfd2022b8845ad8f792aa5825,
    0xa9f746462d870fdf8a65dc1f90e061e5,
    0x70d869a156d2a1b890bb3df62baf32f7,
    0x31be135f97d08fd981231505542fcfa6,
    0x9aa508b5b7a84e1c677de54f3e99bc9,
    0x5d6af8dedb81196699c329225ee604,
    0x2216e584f5fa1ea926041bedfe98,
    0x48a170391f7dc42444e8fa2,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3PoolState {
    pub address: Account,
    pub liquidity: u128,
    pub sqrt_price_x96: U256,
    /// `None` until the pool has been initialised.
    pub tick: Option<i32>,
    /// Which side of the pair the queried token is on (0 or 1).
    pub queried_token_index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Position {
    pub account: Account,
    pub liquidity: u128,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub pool: V3PoolState,
}

#[inline]
fn mul_shift(value: U256, multiplier: u128) -> U256 {
    // value <= 2^128 and multiplier < 2^128, so the product fits
    (value * U256::from(multiplier)) >> 128
}

/// Q64.96 sqrt price at `tick` (TickMath.getSqrtRatioAtTick).
pub fn get_sqrt_ratio_at_tick(tick: i32) -> Result<U256, AllocationError> {
    if !(MIN_TICK..=MAX_TICK).contains(&tick) {
        return Err(AllocationError::TickOutOfRange(tick));
    }
    let abs_tick = tick.unsigned_abs();

    let mut ratio = if abs_tick & 0x1 != 0 {
        U256::from(BIT0_RATIO)
    } else {
        U256::one() << 128
    };
    for (bit, multiplier) in BIT_MULTIPLIERS.iter().enumerate() {
        if abs_tick & (0x2 << bit) != 0 {
            ratio = mul_shift(ratio, *multiplier);
        }
    }

    if tick > 0 {
        ratio = U256::MAX / ratio;
    }

    // Q128.128 -> Q64.96, rounding up
    let rounded = if (ratio & Q32_MASK).is_zero() { 0 } else { 1 };
    Ok((ratio >> 32) + U256::from(rounded))
}

fn ordered(a: U256, b: U256) -> (U256, U256) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

/// Token0 delta between two sqrt prices (SqrtPriceMath.getAmount0Delta).
pub fn get_amount0_delta(
    sqrt_ratio_ax96: U256,
    sqrt_ratio_bx96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, AllocationError> {
    let (sqrt_ratio_ax96, sqrt_ratio_bx96) = ordered(sqrt_ratio_ax96, sqrt_ratio_bx96);
    if sqrt_ratio_ax96.is_zero() {
        return Err(AllocationError::ZeroDenominator);
    }

    let numerator1 = U256::from(liquidity) << 96;
    let numerator2 = sqrt_ratio_bx96 - sqrt_ratio_ax96;

    if round_up {
        let inner = mul_div_round_up(numerator1, numerator2, sqrt_ratio_bx96)?;
        mul_div_round_up(inner, U256::one(), sqrt_ratio_ax96)
    } else {
        let product: U512 = numerator1.full_mul(numerator2);
        let inner = product / U512::from(sqrt_ratio_bx96);
        u512_to_u256(inner / U512::from(sqrt_ratio_ax96))
            .map_err(|_| AllocationError::Overflow("amount0 delta"))
    }
}

/// Token1 delta between two sqrt prices (SqrtPriceMath.getAmount1Delta).
pub fn get_amount1_delta(
    sqrt_ratio_ax96: U256,
    sqrt_ratio_bx96: U256,
    liquidity: u128,
    round_up: bool,
) -> Result<U256, AllocationError> {
    let (sqrt_ratio_ax96, sqrt_ratio_bx96) = ordered(sqrt_ratio_ax96, sqrt_ratio_bx96);
    let diff = sqrt_ratio_bx96 - sqrt_ratio_ax96;

    if round_up {
        mul_div_round_up(U256::from(liquidity), diff, Q96)
    } else {
        mul_div_floor(U256::from(liquidity), diff, Q96)
    }
}

impl V3Position {
    fn pool_tick(&self) -> Result<i32, AllocationError> {
        self.pool
            .tick
            .ok_or_else(|| AllocationError::UnknownPoolTick(self.pool.address.clone()))
    }

    /// Amount of token0 represented by this position at the pool's current state.
    pub fn amount0(&self) -> Result<U256, AllocationError> {
        let tick = self.pool_tick()?;
        if tick < self.tick_lower {
            get_amount0_delta(
                get_sqrt_ratio_at_tick(self.tick_lower)?,
                get_sqrt_ratio_at_tick(self.tick_upper)?,
                self.liquidity,
                false,
            )
        } else if tick < self.tick_upper {
            get_amount0_delta(
                self.pool.sqrt_price_x96,
                get_sqrt_ratio_at_tick(self.tick_upper)?,
                self.liquidity,
                false,
            )
        } else {
            Ok(U256::zero())
        }
    }

    /// Amount of token1 represented by this position at the pool's current state.
    pub fn amount1(&self) -> Result<U256, AllocationError> {
        let tick = self.pool_tick()?;
        if tick < self.tick_lower {
            Ok(U256::zero())
        } else if tick < self.tick_upper {
            get_amount1_delta(
                get_sqrt_ratio_at_tick(self.tick_lower)?,
                self.pool.sqrt_price_x96,
                self.liquidity,
                false,
            )
        } else {
            get_amount1_delta(
                get_sqrt_ratio_at_tick(self.tick_lower)?,
                get_sqrt_ratio_at_tick(self.tick_upper)?,
                self.liquidity,
                false,
            )
        }
    }

    /// Amount of the queried token (the side recorded on the pool).
    pub fn token_amount(&self) -> Result<U256, AllocationError> {
        match self.pool.queried_token_index {
            0 => self.amount0(),
            1 => self.amount1(),
            other => Err(AllocationError::InvalidTokenIndex(other)),
        }
    }

    /// Sums the queried-token amounts of positions that all belong to one account.
    pub fn reduce_to_holder(positions: &[V3Position]) -> Result<HolderRecord, AllocationError> {
        let mut accounts: Vec<Account> = positions.iter().map(|p| p.account.clone()).collect();
        accounts.sort();
        accounts.dedup();
        if accounts.len() != 1 {
            return Err(AllocationError::MixedPositionAccounts(accounts));
        }

        let mut total = U256::zero();
        for position in positions {
            total = total
                .checked_add(position.token_amount()?)
                .ok_or(AllocationError::Overflow("position reduction"))?;
        }
        Ok(HolderRecord::new(accounts.remove(0), total))
    }
}
