//! Delivery runs ("loads") and the state machine that moves orders onto,
//! out with, and back from them.

pub mod load;
pub mod run;

pub use load::{
    AssignOrder, CreateLoad, ItemsTransitioned, Load, LoadCommand, LoadCreated, LoadEvent,
    LoadTransition, OrderAssigned, OrderRemoved, RemoveOrder,
};
pub use run::{
    DeliveryItem, DeliveryItemId, DeliveryItemStatus, DeliveryRun, DeliveryRunId, LoadStatus,
    OrderRef, OrderStatusChange, PickingTeamId, generate_run_number,
};
