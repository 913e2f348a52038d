use crate::models::{Collection, Record, ServerId};
use crate::store::WriteTxn;
use crate::Result;

/// The family whose data this device replicates.
///
/// Records that belong to another family are discarded before merging.
/// Items and location points carry no family of their own; they are judged
/// by their parent when the parent is known locally and admitted otherwise,
/// since the server already scoped them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyScope {
    family_id: ServerId,
}

impl FamilyScope {
    pub const fn new(family_id: ServerId) -> Self {
        Self { family_id }
    }

    pub const fn family_id(&self) -> &ServerId {
        &self.family_id
    }

    pub fn admits(&self, txn: &WriteTxn<'_>, record: &Record) -> Result<bool> {
        let family = &self.family_id;
        Ok(match record {
            Record::Family(row) => &row.meta.server_id == family,
            Record::Member(row) => &row.family_id == family,
            Record::List(row) => &row.family_id == family,
            Record::Geofence(row) => &row.family_id == family,
            Record::ListItem(item) => match txn.get_record(Collection::Lists, &item.list_id)? {
                Some(Record::List(list)) => &list.family_id == family,
                _ => true,
            },
            Record::LocationHistory(point) => {
                match txn.get_record(Collection::Members, &point.user_id)? {
                    Some(Record::Member(member)) => &member.family_id == family,
                    _ => true,
                }
            }
        })
    }
}
