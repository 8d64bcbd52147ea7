//! Order (clan) model and its fixed-size record form.

use crate::database::entities::user::ScoreRecord;
use crate::database::record::{self, RecordError, RecordResult};
use crate::utils::types::{OrderId, UserId};
use bytes::{BufMut, Bytes, BytesMut};

/// Signature word marking an order record ('ORDR')
pub const ORDER_RECORD_SIGNATURE: u32 = 0x4f524452;
/// Serialized size of one order record
pub const ORDER_RECORD_SIZE: usize = 512;

/// Sentinel id marking a record slot as unused
pub const UNUSED_ORDER_ID: OrderId = 0xFFFFFFFF;

pub const MAXIMUM_ORDER_NAME_LENGTH: usize = 31;
pub const MAXIMUM_CONTACT_LENGTH: usize = 63;
pub const MAXIMUM_ORDER_PASSWORD_LENGTH: usize = 31;
pub const MAXIMUM_ORDER_MEMBERS: usize = 32;

/// Membership below this for the upkeep threshold duration marks the
/// order unused
pub const MINIMUM_ORDER_MEMBERS: usize = 2;

/// A clan owned by a leader user. Orders are marked unused rather than
/// removed so their ids are never recycled.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    /// Unique name, compared case-insensitively
    pub name: String,
    /// Leader user id
    pub leader: UserId,
    /// Unix seconds the order was founded
    pub founded: i64,
    pub contact_email: String,
    pub maintenance_password: String,
    pub member_password: String,
    pub members: Vec<UserId>,
    /// Unix seconds membership first dropped below the minimum, zero
    /// while the roster is healthy
    pub below_minimum_since: i64,
    pub unranked_score: ScoreRecord,
    pub ranked_score: ScoreRecord,
}

impl Order {
    pub fn is_unused(&self) -> bool {
        self.id == UNUSED_ORDER_ID
    }

    /// Serializes this order into its fixed-size record form
    pub fn to_record(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(ORDER_RECORD_SIZE);
        dst.put_u32_le(ORDER_RECORD_SIGNATURE);
        dst.put_u32_le(self.id);
        record::write_fixed_string(&mut dst, &self.name, MAXIMUM_ORDER_NAME_LENGTH);
        dst.put_u32_le(self.leader);
        dst.put_i64_le(self.founded);
        record::write_fixed_string(&mut dst, &self.contact_email, MAXIMUM_CONTACT_LENGTH);
        record::write_fixed_string(
            &mut dst,
            &self.maintenance_password,
            MAXIMUM_ORDER_PASSWORD_LENGTH,
        );
        record::write_fixed_string(&mut dst, &self.member_password, MAXIMUM_ORDER_PASSWORD_LENGTH);
        dst.put_u8(self.members.len().min(MAXIMUM_ORDER_MEMBERS) as u8);
        for slot in 0..MAXIMUM_ORDER_MEMBERS {
            dst.put_u32_le(self.members.get(slot).copied().unwrap_or(0));
        }
        dst.put_i64_le(self.below_minimum_since);
        self.unranked_score.write(&mut dst);
        self.ranked_score.write(&mut dst);
        record::write_padding(&mut dst, ORDER_RECORD_SIZE);
        dst
    }

    /// Deserializes an order from its record form
    pub fn from_record(mut src: Bytes) -> RecordResult<Order> {
        let signature = record::read_u32(&mut src)?;
        if signature != ORDER_RECORD_SIGNATURE {
            return Err(RecordError::BadSignature(signature));
        }
        let id = record::read_u32(&mut src)?;
        let name = record::read_fixed_string(&mut src, MAXIMUM_ORDER_NAME_LENGTH)?;
        let leader = record::read_u32(&mut src)?;
        let founded = record::read_i64(&mut src)?;
        let contact_email = record::read_fixed_string(&mut src, MAXIMUM_CONTACT_LENGTH)?;
        let maintenance_password =
            record::read_fixed_string(&mut src, MAXIMUM_ORDER_PASSWORD_LENGTH)?;
        let member_password = record::read_fixed_string(&mut src, MAXIMUM_ORDER_PASSWORD_LENGTH)?;

        let member_count = record::read_u8(&mut src)? as usize;
        if member_count > MAXIMUM_ORDER_MEMBERS {
            return Err(RecordError::OutOfRange("order member count"));
        }
        let mut members = Vec::with_capacity(member_count);
        for slot in 0..MAXIMUM_ORDER_MEMBERS {
            let value = record::read_u32(&mut src)?;
            if slot < member_count {
                members.push(value);
            }
        }

        let below_minimum_since = record::read_i64(&mut src)?;
        let unranked_score = ScoreRecord::read(&mut src)?;
        let ranked_score = ScoreRecord::read(&mut src)?;

        Ok(Order {
            id,
            name,
            leader,
            founded,
            contact_email,
            maintenance_password,
            member_password,
            members,
            below_minimum_since,
            unranked_score,
            ranked_score,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_order() -> Order {
        Order {
            id: 11,
            name: "The Wolves".to_string(),
            leader: 42,
            founded: 1_040_000_000,
            contact_email: "leader@example.net".to_string(),
            maintenance_password: "maint".to_string(),
            member_password: "join-us".to_string(),
            members: vec![42, 51, 60],
            below_minimum_since: 0,
            unranked_score: ScoreRecord::default(),
            ranked_score: ScoreRecord {
                games_played: 12,
                wins: 8,
                points: 20,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_record_round_trip() {
        let order = sample_order();
        let record = order.to_record();
        assert_eq!(record.len(), ORDER_RECORD_SIZE);
        let loaded = Order::from_record(record.clone().freeze()).unwrap();
        assert_eq!(loaded, order);
        assert_eq!(loaded.to_record(), record);
    }

    #[test]
    fn test_unused_sentinel() {
        let mut order = sample_order();
        assert!(!order.is_unused());
        order.id = UNUSED_ORDER_ID;
        assert!(order.is_unused());
    }
}
