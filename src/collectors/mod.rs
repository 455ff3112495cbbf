pub mod forecast_cache;
pub mod open_meteo;
