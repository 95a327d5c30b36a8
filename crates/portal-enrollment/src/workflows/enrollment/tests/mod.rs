mod checkout;
mod common;
mod eligibility;
mod lifecycle;
mod roster;
