pub mod message;
pub mod presence;
pub mod room;

/// Whether an item scoped to `item_group` is visible to a viewer in
/// `viewer_group`.
///
/// Group 0 items are visible to everyone. A viewer in group 0 is not
/// restricted to a group and sees every item in the room.
pub fn visible_to(viewer_group: i64, item_group: i64) -> bool {
    viewer_group == 0 || item_group == 0 || item_group == viewer_group
}
