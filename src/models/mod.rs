pub mod category;
pub mod event;
pub mod extra;
pub mod field_answer;
pub mod promo_code;
pub mod reservation;
pub mod special_price;
pub mod ticket;
pub mod transaction;
