pub mod error;
pub mod market;

#[cfg(test)]
mod test_support;
