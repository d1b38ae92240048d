// src/pages.rs
//! Static entry forms served on the GET side of each form route.

pub const LOGIN: &str = r#"<!DOCTYPE html>
<html><head><title>Log In</title></head><body>
<form action="/login" method="post">
<input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
<input name="password" placeholder="Password" type="password">
<button type="submit">Log In</button>
</form>
<p><a href="/register">Register</a></p>
</body></html>"#;

pub const REGISTER: &str = r#"<!DOCTYPE html>
<html><head><title>Register</title></head><body>
<form action="/register" method="post">
<input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
<input name="password" placeholder="Password" type="password">
<input name="confirmation" placeholder="Password (again)" type="password">
<button type="submit">Register</button>
</form>
</body></html>"#;

pub const QUOTE: &str = r#"<!DOCTYPE html>
<html><head><title>Quote</title></head><body>
<form action="/quote" method="post">
<input autocomplete="off" autofocus name="stock_symbol" placeholder="Symbol" type="text">
<button type="submit">Quote</button>
</form>
</body></html>"#;

pub const BUY: &str = r#"<!DOCTYPE html>
<html><head><title>Buy</title></head><body>
<form action="/buy" method="post">
<input autocomplete="off" autofocus name="stock_symbol" placeholder="Symbol" type="text">
<input min="1" name="shares" placeholder="Shares" type="number">
<button type="submit">Buy</button>
</form>
</body></html>"#;

pub const ADD_CASH: &str = r#"<!DOCTYPE html>
<html><head><title>Add Cash</title></head><body>
<form action="/add_cash" method="post">
<input autocomplete="off" autofocus name="cash" placeholder="Amount" type="text">
<button type="submit">Add Cash</button>
</form>
</body></html>"#;
