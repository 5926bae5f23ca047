use serde::Deserialize;
use tracing::warn;

use crate::config::WeatherConfig;

/// OpenWeather REST client. Network failures and non-2xx responses degrade
/// to `None`/empty and never raise past this boundary. The agent's tools
/// turn a `None` into an explanatory sentence for the model.
pub struct OpenWeather {
    client: reqwest::Client,
    api_key: String,
    geo_url: String,
    weather_url: String,
    forecast_url: String,
}

/// One geocoding result: a place name resolved to coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoLocation {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub country: Option<String>,
}

impl OpenWeather {
    pub fn new(config: &WeatherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone().unwrap_or_default(),
            geo_url: config.geo_url.clone(),
            weather_url: config.weather_url.clone(),
            forecast_url: config.forecast_url.clone(),
        }
    }

    /// Resolve a city name (optionally qualified by a two-letter country
    /// code) to coordinates. Empty when nothing matched or the call failed.
    pub async fn get_geolocation(
        &self,
        city: &str,
        country_code: Option<&str>,
    ) -> Vec<GeoLocation> {
        let query = match country_code {
            Some(code) => format!("{city},{code}"),
            None => city.to_string(),
        };

        let response = self
            .client
            .get(&self.geo_url)
            .query(&[("q", query.as_str()), ("limit", "1"), ("appid", &self.api_key)])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                resp.json::<Vec<GeoLocation>>().await.unwrap_or_default()
            }
            Ok(resp) => {
                warn!(city, status = %resp.status(), "geocoding request rejected");
                Vec::new()
            }
            Err(e) => {
                warn!(city, "geocoding request failed: {e}");
                Vec::new()
            }
        }
    }

    /// Current conditions at a coordinate, metric units.
    pub async fn get_current_weather(&self, lat: f64, lon: f64) -> Option<serde_json::Value> {
        self.fetch_json(&self.weather_url, lat, lon, None).await
    }

    /// 5-day / 3-hour forecast at a coordinate (40 entries), metric units.
    pub async fn get_forecast(&self, lat: f64, lon: f64) -> Option<serde_json::Value> {
        self.fetch_json(&self.forecast_url, lat, lon, Some(40)).await
    }

    async fn fetch_json(
        &self,
        url: &str,
        lat: f64,
        lon: f64,
        cnt: Option<u32>,
    ) -> Option<serde_json::Value> {
        let mut params = vec![
            ("lat", lat.to_string()),
            ("lon", lon.to_string()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
            ("lang", "en".to_string()),
        ];
        if let Some(cnt) = cnt {
            params.push(("cnt", cnt.to_string()));
        }

        let response = self.client.get(url).query(&params).send().await;
        match response {
            Ok(resp) if resp.status().is_success() => resp.json().await.ok(),
            Ok(resp) => {
                warn!(url, status = %resp.status(), "weather request rejected");
                None
            }
            Err(e) => {
                warn!(url, "weather request failed: {e}");
                None
            }
        }
    }
}

fn fmt_time(epoch: Option<i64>) -> String {
    match epoch.and_then(|e| chrono::DateTime::from_timestamp(e, 0)) {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => "N/A".to_string(),
    }
}

fn num(value: &serde_json::Value, path: &[&str]) -> String {
    let mut current = value;
    for key in path {
        match current.get(*key) {
            Some(v) => current = v,
            None => return "N/A".to_string(),
        }
    }
    match current {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => "N/A".to_string(),
    }
}

/// Render a current-weather payload as readable markdown.
pub fn format_current_weather(
    data: &serde_json::Value,
    city: &str,
    country_code: Option<&str>,
) -> String {
    let country = country_code
        .map(String::from)
        .or_else(|| {
            data.get("sys")
                .and_then(|s| s.get("country"))
                .and_then(|c| c.as_str())
                .map(String::from)
        })
        .map(|c| format!(", {c}"))
        .unwrap_or_default();

    let condition = data
        .get("weather")
        .and_then(|w| w.get(0))
        .cloned()
        .unwrap_or_default();
    let updated = fmt_time(data.get("dt").and_then(|d| d.as_i64()));
    let sunrise = fmt_time(
        data.get("sys")
            .and_then(|s| s.get("sunrise"))
            .and_then(|v| v.as_i64()),
    );
    let sunset = fmt_time(
        data.get("sys")
            .and_then(|s| s.get("sunset"))
            .and_then(|v| v.as_i64()),
    );

    format!(
        "📍 Current Weather in {city}{country}\n\
         ⏰ Updated: {updated}\n\
         📌 Coordinates: Lat {lat}, Lon {lon}\n\n\
         🌡️ Temperature: {temp}°C (feels like {feels}°C, min {min}°C, max {max}°C)\n\
         🌤️ Condition: {cond_main} — {cond_desc}\n\
         💧 Humidity: {humidity}%\n\
         🧭 Pressure: {pressure} hPa\n\
         💨 Wind: {wind_speed} m/s at {wind_deg}°\n\
         ☁️ Cloudiness: {clouds}%\n\
         🌅 Sunrise: {sunrise}\n\
         🌇 Sunset: {sunset}",
        lat = num(data, &["coord", "lat"]),
        lon = num(data, &["coord", "lon"]),
        temp = num(data, &["main", "temp"]),
        feels = num(data, &["main", "feels_like"]),
        min = num(data, &["main", "temp_min"]),
        max = num(data, &["main", "temp_max"]),
        cond_main = condition.get("main").and_then(|v| v.as_str()).unwrap_or("N/A"),
        cond_desc = condition
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A"),
        humidity = num(data, &["main", "humidity"]),
        pressure = num(data, &["main", "pressure"]),
        wind_speed = num(data, &["wind", "speed"]),
        wind_deg = num(data, &["wind", "deg"]),
        clouds = num(data, &["clouds", "all"]),
    )
}

/// Render a 5-day forecast payload as readable markdown, sampling one entry
/// per day (every 8th 3-hour slot).
pub fn format_forecast(
    data: &serde_json::Value,
    city: &str,
    country_code: Option<&str>,
) -> String {
    let entries = match data.get("list").and_then(|l| l.as_array()) {
        Some(list) if !list.is_empty() => list,
        _ => return format!("No forecast data available for {city}"),
    };

    let country = country_code
        .map(String::from)
        .or_else(|| {
            data.get("city")
                .and_then(|c| c.get("country"))
                .and_then(|c| c.as_str())
                .map(String::from)
        })
        .map(|c| format!(", {c}"))
        .unwrap_or_default();

    let mut out = format!("📅 5-Day Weather Forecast for {city}{country}\n");

    for entry in entries.iter().step_by(8).take(5) {
        let when = entry
            .get("dt")
            .and_then(|d| d.as_i64())
            .and_then(|e| chrono::DateTime::from_timestamp(e, 0))
            .map(|dt| dt.format("%A, %b %d, %Y at %H:%M").to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let condition = entry
            .get("weather")
            .and_then(|w| w.get(0))
            .cloned()
            .unwrap_or_default();

        out.push_str(&format!(
            "\n📆 {when}\n\
             🌡️ Temperature: {temp}°C (feels like {feels}°C, min {min}°C, max {max}°C)\n\
             🌤️ Condition: {cond_main} — {cond_desc}\n\
             💧 Humidity: {humidity}%\n\
             💨 Wind: {wind_speed} m/s at {wind_deg}°\n\
             ☁️ Cloudiness: {clouds}%\n",
            temp = num(entry, &["main", "temp"]),
            feels = num(entry, &["main", "feels_like"]),
            min = num(entry, &["main", "temp_min"]),
            max = num(entry, &["main", "temp_max"]),
            cond_main = condition.get("main").and_then(|v| v.as_str()).unwrap_or("N/A"),
            cond_desc = condition
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("N/A"),
            humidity = num(entry, &["main", "humidity"]),
            wind_speed = num(entry, &["wind", "speed"]),
            wind_deg = num(entry, &["wind", "deg"]),
            clouds = num(entry, &["clouds", "all"]),
        ));

        if let Some(pop) = entry.get("pop").and_then(|p| p.as_f64()) {
            out.push_str(&format!("🌧️ Chance of precipitation: {:.0}%\n", pop * 100.0));
        }
    }

    out
}
